mod common;
mod deploy_tests;
mod synth_tests;
