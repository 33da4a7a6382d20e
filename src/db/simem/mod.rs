pub mod agents;
pub mod contracts;
pub mod lib_simem;
pub mod public_data_archive;
pub mod relational;
