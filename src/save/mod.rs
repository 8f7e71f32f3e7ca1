//! Draft saving: the section queue, record building and the controller
//! that schedules and retries `cxsave` requests.

mod controller;
mod metrics;
mod queue;
mod records;

pub use controller::{
    FlushDecision, FlushTrigger, PreparedSave, SaveController, SaveError, SaveReceipt,
    SaveSettings, ABUSE_FILTER_TITLE_KEY, UNSAVED_WARNING_KEY,
};
pub use metrics::{SaveMetrics, SaveMetricsReport};
pub use queue::{SaveQueue, SectionPayload, SourcePayload, TranslationPayload};
pub use records::{origin_for_provider, SectionRecord, SOURCE_ORIGIN, USER_ORIGIN};
