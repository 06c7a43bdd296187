#![allow(unused_macros)]

/// Helper macro for locking items
///
/// A poisoned mutex is recovered: the guarded data is only ever replaced as a whole.
///
/// ```rust, ignore
///  let mut archive = lock!(self.archive);
///  let entry = archive.by_name("a/B.class")?;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let resolvers = read_lock!(self.resolvers);
///  println!("{}", resolvers.len());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  write_lock!(self.resolvers).push(resolver);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}
