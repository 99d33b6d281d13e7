pub mod command;
pub mod path_validator;
