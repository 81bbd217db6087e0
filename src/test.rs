mod change_stream;
mod cursor;
mod topology;
pub(crate) mod util;
