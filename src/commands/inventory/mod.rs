pub mod adjust_stock_command;
pub mod set_stock_levels_command;
