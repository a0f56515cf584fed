use std::sync::Arc;

use crate::auth::AuthManager;
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::db::DbPool;
use crate::fanout::NotificationFanout;
use crate::hub::RoomHub;
use crate::store::{GroupDirectory, MessageStore};

/// Application context containing shared dependencies.
/// This reduces parameter passing and makes it easier to add new dependencies.
#[derive(Clone)]
pub struct AppContext {
    pub db_pool: DbPool,
    pub store: MessageStore,
    pub directory: GroupDirectory,
    pub hub: Arc<RoomHub>,
    pub broadcaster: Broadcaster,
    pub fanout: Arc<NotificationFanout>,
    pub auth_manager: Arc<AuthManager>,
    pub config: Arc<Config>,
}
