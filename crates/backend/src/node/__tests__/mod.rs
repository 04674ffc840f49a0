mod node;
mod supervisor;
