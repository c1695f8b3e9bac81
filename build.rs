fn main() {
    // ESP-IDF link arguments only exist when building for the device;
    // host builds (simulator, tests) have nothing to forward.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
