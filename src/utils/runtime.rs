use anyhow::Result;

/// The daemon is a single logical thread of control, so it runs on a current thread runtime.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
