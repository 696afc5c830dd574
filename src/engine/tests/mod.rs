pub mod helpers;
mod tests_lifecycle;
mod tests_recovery;
