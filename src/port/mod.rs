pub mod midi_usb;
pub mod serial;
