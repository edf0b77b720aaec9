mod index;
mod runtime;
