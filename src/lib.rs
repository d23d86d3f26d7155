//! Blurred dims everything that is not the frontmost application by placing
//! black click-through windows directly beneath it on every display.

pub mod actor;
pub mod common;
pub mod sys;
pub mod ui;
