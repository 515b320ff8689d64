pub(crate) mod events;
pub(crate) mod inspect;
pub(crate) mod probe;
pub(crate) mod scan;
pub(crate) mod targets;
pub(crate) mod user;
