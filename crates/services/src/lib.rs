#![forbid(unsafe_code)]

pub mod action;
pub mod app_services;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod render;
pub mod report_service;
pub mod sessions;
pub mod transport;

pub use trainer_core::Clock;

pub use action::{Action, ActionParseError};
pub use app_services::AppServices;
pub use dispatch::{Dispatcher, Inbound, InboundEvent};
pub use error::{AppServicesError, DispatchError, Recovery, ReportError, SessionError};
pub use messages::{DefaultMessages, MessageCatalog, MessageOverrides, MessageTag, Messages};
pub use render::{Screen, ScreenAction};
pub use report_service::{LearnerReport, OpenAnswerReport, ReportService, TopicReport};
pub use sessions::{LearnerLocks, Outcome, SessionController};
pub use transport::{Transport, TransportError};
