pub mod render;

#[cfg(any(test, feature = "test"))]
pub mod test;
