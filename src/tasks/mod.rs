pub mod accel;
pub mod app;
pub mod display;
pub mod i2c;
pub mod power;
pub mod spi;
pub mod timers;
pub mod worker;
