use minijinja::Environment;
use std::sync::Arc;

use crate::models::allow_list::{AllowList, AllowListError};
use crate::models::form_data::FormStore;
use crate::models::user::UserDirectory;
use crate::realtime::{EventBus, PresenceStore};
use crate::AppConfig;

pub const FORBIDDEN_TEMPLATE: &str = "forbidden.html";

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub env: Environment<'static>,
    /// Parsed once at startup. A bad list is kept as an error so every
    /// request can answer 503 instead of the process refusing to start.
    pub allow_list: Result<AllowList, AllowListError>,
    pub users: UserDirectory,
    pub forms: Arc<dyn FormStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub bus: Arc<dyn EventBus>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        forms: Arc<dyn FormStore>,
        presence: Arc<dyn PresenceStore>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(
            FORBIDDEN_TEMPLATE,
            include_str!("../../templates/forbidden.html"),
        )?;

        let allow_list = config.allowed_ips.parse::<AllowList>();
        let users = UserDirectory::from_config(&config.users);

        Ok(Self {
            config,
            env,
            allow_list,
            users,
            forms,
            presence,
            bus,
            http_client: reqwest::Client::new(),
        })
    }
}
