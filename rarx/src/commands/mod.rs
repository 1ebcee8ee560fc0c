mod extract;
mod info;
mod list;
mod test;

pub use extract::run as extract;
pub use info::run as info;
pub use list::run as list;
pub use test::run as test;
