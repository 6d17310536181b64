#[cfg(unix)]
mod command_pool;
mod runner;
mod start_rollback;
