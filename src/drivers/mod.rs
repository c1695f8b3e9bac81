pub mod lis3dh;
pub mod ssd1306;
pub mod timer_bank;
