//! Unit test target

mod support;

mod test_analyzer;
mod test_env_policy;
mod test_fsm;
mod test_pipeline;
mod test_proxy;
