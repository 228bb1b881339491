mod dead_letter_producer;

pub use dead_letter_producer::*;
