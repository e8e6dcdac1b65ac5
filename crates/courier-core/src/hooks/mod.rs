pub mod events;

pub use events::{HookEvent, HookEventKind, HookRecord};
