fn main() {
    // The Arabic font is loaded at runtime; warn early if the default is absent
    let font_path = "fonts/Amiri-Regular.ttf";
    println!("cargo:rerun-if-changed={}", font_path);

    if !std::path::Path::new(font_path).exists() {
        println!("cargo:warning=Arabic font not found at {}", font_path);
        println!("cargo:warning=Place Amiri-Regular.ttf there or set ARABIC_FONT_PATH before starting the server");
    }
}
