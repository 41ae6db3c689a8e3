pub mod object_dict1;
pub mod sim_bus;
