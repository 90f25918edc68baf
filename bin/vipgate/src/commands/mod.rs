pub mod doctor;
pub mod qr;
pub mod serve;
pub mod webhook;
