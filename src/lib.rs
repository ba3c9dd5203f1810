/*
 * Two-way synchronization between an external launcher's binary shortcuts file and a
 * game library catalog.
 */
pub mod core;
