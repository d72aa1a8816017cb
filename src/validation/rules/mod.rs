pub(crate) mod inputs;
pub(crate) mod targets;
