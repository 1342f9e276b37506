pub mod exec;
pub mod logging;
pub mod privileges;
pub mod string;
