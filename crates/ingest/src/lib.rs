//! Message ingestion and live synchronization.
//!
//! Provider payload → [`normalizer`] → [`IngestPipeline`] (store write) →
//! [`FanoutBus`] (push to viewers). Reads go through
//! [`ConversationAggregator`], which derives summaries from the store on
//! every call.

pub mod aggregator;
pub mod error;
pub mod event;
pub mod fanout;
pub mod normalizer;
pub mod pipeline;
pub mod store;

pub use {
    aggregator::{ConversationAggregator, summarize},
    error::{Error, Result},
    event::{InboundEvent, NewMessageEvent, StatusEvent},
    fanout::{FanoutBus, FanoutEvent, FanoutTopic, Subscription},
    normalizer::{NormalizeReport, fallback_display_name, normalize},
    pipeline::{
        IngestOutcome, IngestPipeline, IngestReport, IngestStats, IngestStatsSnapshot,
        StatusOutcome,
    },
    store::{InMemoryMessageStore, InsertOutcome, MessageStore, StatusChange, StoreClock},
};
