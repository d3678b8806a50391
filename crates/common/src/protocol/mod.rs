// Wire protocol shapes shared between the engine and the edit gateway.

pub mod gateway;
