pub mod board_matcher;
pub mod bus;
pub mod notifier;
pub mod scheduler;
pub mod throttle;
