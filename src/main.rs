mod clipboards;
mod config;
mod controller;
mod error;
mod event;
mod libmain;
mod logging;
mod monitor;
mod rules;
mod tools;

fn main() {
 libmain::main();
}
