//! Path normalization shared by collection and watch mode.

pub mod path;
