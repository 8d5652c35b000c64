mod common;
mod stage;
