pub mod call_leg;
