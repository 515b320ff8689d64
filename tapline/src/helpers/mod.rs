pub(crate) mod logger;
pub(crate) mod signals;
pub(crate) mod time;
