mod list;
mod mapped;
mod scalars;

pub use list::*;
pub use mapped::*;
pub use scalars::*;
