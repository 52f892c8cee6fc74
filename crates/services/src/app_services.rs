use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::dispatch::Dispatcher;
use crate::error::AppServicesError;
use crate::messages::Messages;
use crate::report_service::ReportService;
use crate::sessions::{LearnerLocks, SessionController};

/// Assembles the engine: one controller, its dispatcher, and the staff report
/// service sharing the controller's learner locks.
#[derive(Clone)]
pub struct AppServices {
    storage: Storage,
    controller: Arc<SessionController>,
    dispatcher: Arc<Dispatcher>,
    reports: Arc<ReportService>,
}

impl AppServices {
    #[must_use]
    pub fn new(storage: Storage, clock: Clock, messages: Messages) -> Self {
        let locks = Arc::new(LearnerLocks::new());
        let controller = Arc::new(SessionController::with_locks(
            clock,
            &storage,
            messages,
            Arc::clone(&locks),
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&controller)));
        let reports = Arc::new(ReportService::new(&storage, locks));

        Self {
            storage,
            controller,
            dispatcher,
            reports,
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        messages: Messages,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(storage, clock, messages))
    }

    #[must_use]
    pub fn in_memory(clock: Clock, messages: Messages) -> Self {
        Self::new(Storage::in_memory(), clock, messages)
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn controller(&self) -> Arc<SessionController> {
        Arc::clone(&self.controller)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    #[must_use]
    pub fn reports(&self) -> Arc<ReportService> {
        Arc::clone(&self.reports)
    }
}
