
mod builder_tests;
mod computed_selection_set_tests;
