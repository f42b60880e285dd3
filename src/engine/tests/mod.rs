pub mod helpers;
mod tests_allocation;
