use log::debug;
use reqwest::StatusCode;

use super::MarketError;

pub fn map_any_err_and_code(e: anyhow::Error) -> (StatusCode, String) {
    debug!("Error: {:#}", e);
    let code = match e.downcast_ref::<MarketError>() {
        Some(e) => status_for(e),
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, format!("{:#}", e))
}
pub fn map_any_err(e: anyhow::Error) -> String {
    debug!("Error: {:#}", e);
    format!("{:#}", e)
}
pub fn status_for(e: &MarketError) -> StatusCode {
    match e {
        MarketError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        MarketError::NotFound(_) => StatusCode::NOT_FOUND,
        MarketError::Unauthorized(_) | MarketError::NotEligible(_) => StatusCode::FORBIDDEN,
        MarketError::InvalidState(_)
        | MarketError::WindowClosed { .. }
        | MarketError::AlreadyCompleted(_)
        | MarketError::AlreadyClaimed { .. }
        | MarketError::InsufficientPool { .. } => StatusCode::CONFLICT,
    }
}
