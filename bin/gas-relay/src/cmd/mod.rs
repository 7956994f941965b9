pub(crate) mod run;
pub(crate) mod status;
