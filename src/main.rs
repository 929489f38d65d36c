fn main() {
    excel_consolidator_lib::run()
}
