#[cfg(unix)]
mod e2e;
