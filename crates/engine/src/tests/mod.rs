mod helpers;

mod manifest_tests;
mod write_tests;
