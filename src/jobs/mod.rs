pub mod availability_sync;
