//! Post Assembly Library
//!
//! Turns a time slot into a finished social post:
//! - `schedule` / `dispatch`: resolve (weekday, hour) or a manual override into a routine
//! - `routine`: the registry of assembly variants and their prompt/fallback builders
//! - `selector` + `history`: pick catalog items that have not been posted before
//! - `tags` + `caption`: hashtag cascade and the three-rung caption ladder
//! - `collage` + `compress`: grid compositing and byte-budget JPEG encoding
//! - `post`: the pipeline that wires everything together and publishes
//!
//! Network access lives behind the collaborator traits ([`Catalog`],
//! [`TextGenerator`], [`ImageSource`], [`Publisher`]); this crate never opens
//! a socket itself.

pub mod caption;
pub mod collage;
pub mod compress;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod post;
pub mod routine;
pub mod schedule;
pub mod selector;
pub mod tags;

pub use caption::{
    Caption, CaptionLadder, CaptionLimits, CaptionRequest, CaptionSource, TextGenerator,
};

pub use collage::{compose, CollageLayout, GridMode};
pub use compress::{compress, Compressed, CompressionBudget};
pub use config::{AssemblyConfig, PromoConfig};
pub use content::{ContentItem, ImageAsset};
pub use dispatch::{
    DispatchOutcome, DispatchReport, DispatchRequest, DispatchState, Dispatcher, Resolution,
    RoutineRunner,
};
pub use error::{CollaboratorError, ErrorKind, GenerationError, PipelineError, PipelineResult};
pub use history::{HistoryCategory, HistoryError, HistoryRecord, HistoryStore};
pub use post::{
    AssembledPost, Collaborators, ImageRef, ImageSource, PayloadImage, Pipeline, PostImage,
    PostReceipt, Publisher, RunOutcome,
};
pub use routine::{Routine, RoutineRegistry, SlotId, StarterTheme, Theme, Topic};
pub use schedule::{parse_override, ScheduleTable, SlotEntry};
pub use selector::{CandidateSelector, Catalog, CatalogFilter, DateRange, SelectionLimits};
pub use tags::{PlatformLabel, TagAssembler, TagRules, TagSet};
