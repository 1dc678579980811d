//! Job handler implementations and registry wiring.

mod cleanup;
mod credit;
mod recurring;
mod reminder;
mod streak;
mod subscription;

use std::sync::Arc;

pub use cleanup::ActivityCleanupHandler;
pub use credit::CreditExpireHandler;
pub use recurring::RecurringTaskHandler;
pub use reminder::ReminderFireHandler;
pub use streak::StreakCalculateHandler;
pub use subscription::SubscriptionCheckHandler;

use super::worker::Worker;

/// Register every handler on a worker.
pub fn register_all(worker: &mut Worker) {
    worker.register(Arc::new(ReminderFireHandler));
    worker.register(Arc::new(StreakCalculateHandler));
    worker.register(Arc::new(CreditExpireHandler));
    worker.register(Arc::new(SubscriptionCheckHandler));
    worker.register(Arc::new(RecurringTaskHandler));
    worker.register(Arc::new(ActivityCleanupHandler));
}
