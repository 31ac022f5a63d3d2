// Test module organization
pub mod test_basic;
pub mod test_closures;
pub mod test_compiler;
pub mod test_control_flow;
pub mod test_errors;
pub mod test_functions;
pub mod test_gc;
pub mod test_metamethods;
pub mod test_operators;
pub mod test_table;
