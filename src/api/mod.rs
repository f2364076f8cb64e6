mod error;
mod impls;
mod market;
mod requests;
mod responses;
mod util;

pub use error::*;
pub use impls::*;
pub use market::*;
pub use requests::*;
pub use responses::*;
pub use util::*;
