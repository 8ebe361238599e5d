fn main() {
    lasermount_lib::run()
}
