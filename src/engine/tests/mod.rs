pub mod helpers;
mod tests_model;
mod tests_threshold;
