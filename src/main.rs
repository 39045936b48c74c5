fn main() {
    streamchat_lib::run()
}
