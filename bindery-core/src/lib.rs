mod argument;
mod bind;
mod category;
mod connection;
mod driver;
mod error;
mod input;
mod leak;
mod options;
mod output;
mod pipe;
mod rows;
mod scheduler;
mod slot;
mod statement;
mod transaction;
mod util;
mod value;

pub use ::anyhow::{self, Context};
pub use argument::*;
pub use bind::*;
pub use category::*;
pub use connection::*;
pub use driver::*;
pub use error::*;
pub use input::*;
pub use leak::*;
pub use options::*;
pub use output::*;
pub use pipe::*;
pub use rows::*;
pub use scheduler::*;
pub(crate) use slot::*;
pub use statement::*;
pub use transaction::*;
pub use util::*;
pub use value::*;
