pub mod pickems;
