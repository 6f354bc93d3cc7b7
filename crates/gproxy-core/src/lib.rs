pub mod auth;
pub mod bootstrap;
pub mod dispatch;
pub mod state;

pub use auth::check_api_key;
pub use bootstrap::{Bootstrap, CliArgs, bootstrap, bootstrap_from_env, AGENT_PAGE_PATH};
pub use dispatch::{ProxyBody, ProxyResponse, RequestHandler};
pub use state::AppState;
