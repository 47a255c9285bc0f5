use crate::check::Checker;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub checker: Checker,
    pub pool: Pool,
}
