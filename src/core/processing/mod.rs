pub mod bands;
pub mod chunks;
pub mod color;
pub mod composite;
pub mod indices;
pub mod pipeline;
pub mod save;
pub mod stack;
