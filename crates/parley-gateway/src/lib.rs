pub mod connection;
pub mod dispatcher;
pub mod handlers;
pub mod media;

use std::sync::Arc;

use parley_db::Database;

use crate::dispatcher::Dispatcher;
use crate::media::MediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub media: MediaStore,
    pub jwt_secret: String,
}
