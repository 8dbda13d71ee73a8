fn main() {
    // Only the firmware build needs the ESP-IDF environment; host builds
    // (tests, fuzzing) compile the library alone.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
