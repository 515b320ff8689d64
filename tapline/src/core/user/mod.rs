pub(crate) mod proc;
