mod materials;
