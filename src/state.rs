use std::sync::Arc;

use crate::config::Config;
use crate::convert::Converter;
use crate::db::Store;
use crate::notify::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub converter: Arc<dyn Converter>,
    pub notifier: Notifier,
}
