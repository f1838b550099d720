mod cancel;
